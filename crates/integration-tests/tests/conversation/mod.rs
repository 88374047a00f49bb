mod errors;
mod functions;
mod streaming;
