mod common;

mod ask_api_test;
