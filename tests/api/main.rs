// fn main not required
mod commands;
mod health_check;
mod helpers;
mod messages;
mod reporting;

// integration tests are compiled as a single binary (tests/api/main.rs and its
// submodules) rather than one binary per file, so the linking phase — the
// slow, sequential part — only happens once per `cargo test` run.
