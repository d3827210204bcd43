#![allow(missing_docs)]

mod support;

mod invariants;
mod scenarios;
