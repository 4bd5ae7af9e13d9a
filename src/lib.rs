#![forbid(unsafe_code)]

pub mod alert;
pub mod auth;
pub mod builder;
pub mod bus;
pub mod cap;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod connection;
pub mod coords;
pub mod error;
pub mod geometry;
pub mod http;
pub mod message;
pub mod motion;
pub mod sections;
pub mod store;
pub mod stream;
pub mod ugc;
pub mod vtec;
pub mod wmo;
pub mod zones;

pub use alert::Alert;
pub use builder::{Builder, Disposition};
pub use config::Config;
pub use connection::Connection;
pub use error::{Error, Result};
pub use message::Stanza;
pub use store::Store;
pub use stream::{ConnectionState, IngestStream, StreamEvent};
