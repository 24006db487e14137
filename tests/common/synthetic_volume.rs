use ndarray::Array3;
use phantom_bmd::Volume;

/// A rod: center column, center row, radius and intensity.
pub struct Rod {
    pub cx: usize,
    pub cy: usize,
    pub radius: usize,
    pub value: i16,
}

/// Volume of `depth` axial slices, `background` everywhere except inside the rods,
/// which run through every slice.
pub fn phantom(width: usize, height: usize, depth: usize, background: i16, rods: &[Rod]) -> Volume<i16> {
    let data = Array3::from_shape_fn((depth, height, width), |(_, y, x)| {
        rods.iter()
            .find(|rod| {
                let dx = x as i64 - rod.cx as i64;
                let dy = y as i64 - rod.cy as i64;
                dx * dx + dy * dy <= (rod.radius * rod.radius) as i64
            })
            .map_or(background, |rod| rod.value)
    });
    Volume::new(data, (0.3, 0.3, 1.0), (-50.0, -60.0, 12.5))
}
