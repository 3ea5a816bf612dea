pub mod client; // REST transport for the events and assets listings
pub mod models;
#[cfg(test)]
pub mod scripted; // Testing utilities

pub use client::{ImageSource, OpenSeaClient, PageFetcher};
pub use models::{AssetsPage, EventsPage};
