pub mod debug;
pub mod err;
pub mod info;
pub mod pprint;
pub mod smap;
