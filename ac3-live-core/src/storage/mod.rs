pub mod encoded_writer;
pub mod metadata;
