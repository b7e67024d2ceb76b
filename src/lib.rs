pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod image_ref;
pub mod store;
pub mod tabs;
pub mod translator;
pub mod watch;
pub mod tasks {
    pub mod busy;
    pub mod cloud_query;
    pub mod load_guard;
    pub mod loader;
    pub mod viewport;
}
pub mod platform {
    pub mod unload_guard;
}

pub use controller::{EditorController, MountOptions};
