pub mod recording;
pub mod transcripts;
