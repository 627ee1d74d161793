pub mod segment_map;
pub mod target;

pub use segment_map::{
    segment_distance, Association, DistanceMeasurement, MapModel, MapSegment, NearestFeature,
    ProjectedEndpoint, ProjectedSegment, SegmentDistance,
};
pub use target::square_corners;
