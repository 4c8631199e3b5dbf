pub mod validate_operations;
