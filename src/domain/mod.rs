// Domain layer: models and ports. Nothing here talks to a tool or the network.

pub mod model;
pub mod ports;
