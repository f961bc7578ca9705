pub mod data;
pub mod dist;
pub mod features;
pub mod linear;
pub mod model;
pub mod plot;
pub mod reformat;
pub mod report;
pub mod split;
pub mod stats;
