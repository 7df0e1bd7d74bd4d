pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod navigation;
pub mod playlist;
pub mod sources;
pub mod processing {
    pub mod decode;
    pub mod layout;
}
pub mod tasks {
    pub mod input;
    pub mod preloader;
    pub mod slideshow;
    pub mod viewer;
}
