mod runner;
mod staging;
