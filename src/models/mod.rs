//! Core data models for the image gateway.
//!
//! Objects are addressed by validated `ObjectPath`s; fetches optionally carry a
//! `TransformRequest` naming a derivative of a raster original.

pub mod object;
pub mod transform;
