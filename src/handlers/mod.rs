pub mod beverages;
pub mod images;
pub mod settings;
