mod proxy;
mod upload;

pub use proxy::{ChunkSink, ContentRange, HttpsProxy, ProxyTls};
pub use upload::{CHUNK_SIZE, ImageUpload, ImageUploader};
