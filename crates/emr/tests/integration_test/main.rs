//! Integration tests for phantom-emr.
//!
//! The cluster, stack and object-store control planes are in-memory fakes;
//! no AWS credentials are needed.

mod cluster;
mod fakes;
mod submit;
