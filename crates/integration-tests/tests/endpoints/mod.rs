mod frontend_settings;
mod health;
