// Pipeline processing: pivot, translation, reclassification, labeling and the final pass

pub mod binning;
pub mod crosswalk;
pub mod dictionary;
pub mod export;
pub mod impute;
pub mod inflation;
pub mod pivot;
pub mod shock;
pub mod translate;
