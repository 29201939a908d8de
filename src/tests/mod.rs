mod common;
mod program_test;
