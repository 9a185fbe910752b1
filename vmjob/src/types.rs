use uuid::Uuid;

pub type JobId = Uuid;
pub type Port = u16;
pub type OutputBlob = bytes::Bytes;
