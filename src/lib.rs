#![recursion_limit = "256"]
//! Neural networks assembled from JSON schemas.
//!
//! A schema describes an input or output value; every variable in
//! it becomes a component that converts host values to tensors,
//! encodes them, and (for outputs) decodes and scores predictions.
//! `ml::graph::SchemaGraph` wires two component trees into a
//! trainable graph; `application::driver` serves it over
//! line-delimited JSON.

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
