pub mod ap235;
