mod admin;
mod gateway;
mod helpers;
mod payments;
