//! Payload formats that are not audio codecs

pub mod telephone_event;
