pub mod gdpr;

pub use gdpr::{ConsentDescriptor, RegulationFlag};
