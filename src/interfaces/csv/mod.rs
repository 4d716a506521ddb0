pub mod operation_writer;
pub mod scenario_reader;
