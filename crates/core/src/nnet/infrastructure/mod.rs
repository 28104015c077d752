pub mod epoch_validator;
