pub mod value_label;

pub use self::value_label::ValueLabel;
