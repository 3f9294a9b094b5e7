pub mod request;
pub mod upload;

pub use request::ClassificationRequest;
pub use upload::UploadedFile;
