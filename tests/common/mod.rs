#![allow(dead_code)]

pub mod collaborators;
pub mod database;
pub mod engine;
pub mod harness;

pub use engine::{Outcome, Script, ScriptedEngine, Step, chunk, reply_steps};
pub use harness::{OPENAI_CREDENTIAL_ID, PROJECT_ID, TestHarness};
