mod helpers;
mod tags;
