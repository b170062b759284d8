pub mod client;
pub mod record;

pub use client::{
    ClientConfig, ClientError, ClientFuture, ImportBody, ImportClient, ImportRequest, MSGPACK_GZ,
};
pub use record::{Event, Value};
