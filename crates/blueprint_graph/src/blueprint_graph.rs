//! Data model for blueprint graphs: values, pins, node templates, composed
//! assets and reusable fragments.
//!
//! This crate is pure data plus validation helpers; the composer, registries
//! and execution engine live in `blueprint_engine`.

pub mod asset;
pub mod fragment;
pub mod pin;
pub mod template;
pub mod value;

pub use asset::{
    pin_key, BlueprintAsset, BlueprintConnection, BlueprintNode, BlueprintVariable, VariableScope,
};
pub use fragment::{BoundaryPin, Fragment};
pub use pin::{CoercionTable, DataType, Pin, PinDirection, PinKind};
pub use template::{NodeTemplate, TemplateError};
pub use value::{ObjectId, ObjectRef, Value, ValueConversionError};
