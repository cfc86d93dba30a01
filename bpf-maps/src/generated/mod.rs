#![allow(dead_code, non_camel_case_types, non_snake_case, clippy::all)]

mod linux_bindings;

pub use linux_bindings::*;
