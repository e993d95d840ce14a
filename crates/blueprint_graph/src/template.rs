//! Node templates: the immutable contract a node instance must satisfy.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::pin::{DataType, Pin, PinDirection, PinKind};

/// Definition of a node type, registered once per process run
///
/// A template is immutable after registration; the executor it maps to is
/// held by the registry, not the template, so the document stays pure data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    /// Unique identifier (e.g. "core/Branch" or "pathfind/FindRoute")
    pub template_id: String,
    /// Human-readable display name
    pub name: String,
    /// Category for organization (e.g. "Flow", "Math")
    #[serde(default)]
    pub category: String,
    /// Loop constructs may re-enqueue their own control output; the composer
    /// lets control cycles pass through them and the engine bounds their
    /// iteration count
    #[serde(default)]
    pub loop_construct: bool,
    /// Pin contract for instances of this template
    pub pins: Vec<Pin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeTemplate {
    /// A template with no control pins is pure: it never appears in control
    /// flow and is evaluated on demand when its data outputs are pulled.
    pub fn is_pure(&self) -> bool {
        !self.pins.iter().any(Pin::is_control)
    }

    pub fn input_pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins
            .iter()
            .filter(|p| p.direction == PinDirection::Input)
    }

    pub fn output_pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins
            .iter()
            .filter(|p| p.direction == PinDirection::Output)
    }

    pub fn control_input(&self) -> Option<&Pin> {
        self.input_pins().find(|p| p.is_control())
    }

    pub fn control_outputs(&self) -> impl Iterator<Item = &Pin> {
        self.output_pins().filter(|p| p.is_control())
    }

    pub fn data_inputs(&self) -> impl Iterator<Item = &Pin> {
        self.input_pins().filter(|p| p.is_data())
    }

    pub fn data_outputs(&self) -> impl Iterator<Item = &Pin> {
        self.output_pins().filter(|p| p.is_data())
    }

    pub fn pin(&self, id: &str) -> Option<&Pin> {
        self.pins.iter().find(|p| p.id == id)
    }

    /// Structural check applied at registration time
    pub fn validate(&self) -> Result<(), TemplateError> {
        let mut seen = HashSet::new();
        for pin in &self.pins {
            if !seen.insert(pin.id.as_str()) {
                return Err(TemplateError::DuplicatePin {
                    template_id: self.template_id.clone(),
                    pin_id: pin.id.clone(),
                });
            }
            match pin.kind {
                PinKind::Control => {
                    if pin.data_type != DataType::None {
                        return Err(TemplateError::ControlPinWithType {
                            template_id: self.template_id.clone(),
                            pin_id: pin.id.clone(),
                        });
                    }
                }
                PinKind::Data => {
                    if pin.data_type == DataType::None {
                        return Err(TemplateError::DataPinWithoutType {
                            template_id: self.template_id.clone(),
                            pin_id: pin.id.clone(),
                        });
                    }
                }
            }
        }

        // At most one control input. Zero is legal both for pure nodes (no
        // control pins at all) and for event-style entry nodes (control
        // outputs only).
        let control_ins = self.input_pins().filter(|p| p.is_control()).count();
        if control_ins > 1 {
            return Err(TemplateError::ControlInputCount {
                template_id: self.template_id.clone(),
                found: control_ins,
            });
        }
        Ok(())
    }
}

/// Structural violation in a node template
#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    #[error("template '{template_id}' declares pin '{pin_id}' more than once")]
    DuplicatePin {
        template_id: String,
        pin_id: String,
    },

    #[error("template '{template_id}' must have exactly one control input, found {found}")]
    ControlInputCount { template_id: String, found: usize },

    #[error("control pin '{pin_id}' on template '{template_id}' must not declare a data type")]
    ControlPinWithType {
        template_id: String,
        pin_id: String,
    },

    #[error("data pin '{pin_id}' on template '{template_id}' must declare a data type")]
    DataPinWithoutType {
        template_id: String,
        pin_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_template() -> NodeTemplate {
        NodeTemplate {
            template_id: "core/Branch".to_string(),
            name: "Branch".to_string(),
            category: "Flow".to_string(),
            loop_construct: false,
            pins: vec![
                Pin::control_in(),
                Pin::data_in("condition", DataType::Bool),
                Pin::control_out("then"),
                Pin::control_out("else"),
            ],
            description: None,
        }
    }

    #[test]
    fn valid_template_passes() {
        assert!(branch_template().validate().is_ok());
    }

    #[test]
    fn pure_template_has_no_control_pins() {
        let add = NodeTemplate {
            template_id: "core/Add".to_string(),
            name: "Add".to_string(),
            category: "Math".to_string(),
            loop_construct: false,
            pins: vec![
                Pin::data_in("a", DataType::Float),
                Pin::data_in("b", DataType::Float),
                Pin::data_out("sum", DataType::Float),
            ],
            description: None,
        };
        assert!(add.is_pure());
        assert!(add.validate().is_ok());
        assert!(!branch_template().is_pure());
    }

    #[test]
    fn duplicate_pin_rejected() {
        let mut t = branch_template();
        t.pins.push(Pin::control_out("then"));
        assert!(matches!(
            t.validate(),
            Err(TemplateError::DuplicatePin { .. })
        ));
    }

    #[test]
    fn two_control_inputs_rejected() {
        let mut t = branch_template();
        t.pins.push(Pin {
            id: "run2".to_string(),
            ..Pin::control_in()
        });
        assert!(matches!(
            t.validate(),
            Err(TemplateError::ControlInputCount { found: 2, .. })
        ));
    }

    #[test]
    fn data_pin_without_type_rejected() {
        let mut t = branch_template();
        t.pins.push(Pin {
            id: "broken".to_string(),
            name: "broken".to_string(),
            direction: PinDirection::Input,
            kind: PinKind::Data,
            data_type: DataType::None,
            default: None,
        });
        assert!(matches!(
            t.validate(),
            Err(TemplateError::DataPinWithoutType { .. })
        ));
    }
}
