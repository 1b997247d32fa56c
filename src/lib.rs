pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod logging;
pub mod settings;
pub mod storage;
pub mod web;
pub mod processing {
    pub mod color;
    pub mod decode;
}
pub mod render {
    pub mod panel;
    pub mod presenter;
    pub mod screens;
}
pub mod tasks {
    pub mod control;
    pub mod session;
    pub mod slideshow;
}
