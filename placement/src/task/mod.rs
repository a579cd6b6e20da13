//! Background tasks for the continuous pipeline.

pub(crate) mod janitor;
