//! Hydroloop: closed-loop controller for one recirculating hydroponic system
//!
//! Every tick samples water chemistry, drives the system-specific actuation
//! cycle, doses pH and nutrients toward their setpoints, scores root-zone
//! health and raises alerts. Maintenance scheduling and reporting run on the
//! accumulated history. [`controller::Controller`] is the entry point.

pub mod alerts;
pub mod chemistry;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod error;
pub mod handlers;
pub mod history;
pub mod maintenance;
pub mod models;
pub mod ports;
pub mod profile;
pub mod reporting;
pub mod root_zone;
pub mod sensor;
pub mod system;
pub mod validation;
pub mod websocket;
