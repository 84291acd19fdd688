pub mod image_upload;

pub use image_upload::ImageUpload;
