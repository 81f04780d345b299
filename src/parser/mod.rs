pub mod assemble;
pub mod dom;
pub mod extract;
pub mod layout;
