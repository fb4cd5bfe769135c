pub mod capture;
pub mod compare;
pub mod doctor;
pub mod sections;
pub mod validate;
