pub mod processed_events;

pub use processed_events::ProcessedEventsRepository;
