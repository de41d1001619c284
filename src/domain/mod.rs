pub mod alert;
pub mod node;
