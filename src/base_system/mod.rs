#![allow(dead_code)]

pub mod config;
pub mod context;
pub mod file_utils;
pub mod logging;
