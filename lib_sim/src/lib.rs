// This file is part of the project for the module CS3235 by Prateek
// Copyright 2023 Ruishi Li, Bo Wang, and Prateek Saxena.
// Please do not distribute.

pub mod config;
pub mod event;
pub mod output;
pub mod scheduler;
pub mod setup;
pub mod simulator;
