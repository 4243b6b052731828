mod common;
mod executor;
mod tracking;
