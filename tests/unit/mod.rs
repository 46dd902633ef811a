mod config_tests;
mod pipeline_tests;
