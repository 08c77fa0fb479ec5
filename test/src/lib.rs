//! Test helpers for driving a netsync server and client against an
//! in-memory scene and transport.

pub mod helpers;
