// src/engine/mod.rs

pub(crate) mod zmtp;

pub(crate) use zmtp::{EngineStatus, ZmtpEngine};
