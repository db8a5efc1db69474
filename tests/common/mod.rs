#![allow(dead_code)]

pub mod hdf5_builder;
