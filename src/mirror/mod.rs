pub mod config;
pub mod cycle;
pub mod naming;
pub mod ops;
pub mod overseer;
pub mod result_error;
pub mod scheduler;
pub mod timer;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
