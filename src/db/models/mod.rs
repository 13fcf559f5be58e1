pub mod processed_event_models;

pub use processed_event_models::ProcessedEvent;
