
mod repository;
