// Typed error taxonomy
pub mod error;

// Bearer credential, token sources and renewal
pub mod credentials;

// Two-step identity exchange
pub mod auth;

// Device listing and high-activity trigger
pub mod device;

// Measurement model and shared cache
pub mod measurement;

// Push subscription, SSE framing and payload decoding
pub mod stream;

// Supervised ingestion loop
pub mod pipeline;

// Prometheus rendering
pub mod metrics;

// HTTP API
pub mod api;

// Configuration
pub mod config;
