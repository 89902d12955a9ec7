pub mod core;
pub mod plugins;

pub use self::core::{
    config::{Credentials, SessionConfig},
    errors::BitexError,
    request::{PreparedRequest, Request},
    response::{BitexResponse, ResponseFormat},
    session::{RequestOptions, Session},
    shorthand::{Endpoint, ShorthandMatch},
    types::*,
};
pub use plugins::{Plugin, PluginAnnouncement, PluginRegistry};

#[doc(hidden)]
pub use inventory;
