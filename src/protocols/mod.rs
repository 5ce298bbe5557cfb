pub mod ivi_input;
