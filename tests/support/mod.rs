#![allow(dead_code)]

pub mod range_server;
