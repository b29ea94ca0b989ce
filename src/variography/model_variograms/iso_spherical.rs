use super::IsoVariogramModel;

#[derive(Debug, Clone, Default, Copy, PartialEq)]
pub struct IsoSpherical {
    pub range: f64,
    pub sill: f64,
}

impl IsoSpherical {
    pub fn new(range: f64, sill: f64) -> Self {
        Self { range, sill }
    }
}

impl IsoVariogramModel for IsoSpherical {
    fn c_0(&self) -> f64 {
        self.sill
    }

    fn variogram(&self, h: f64) -> f64 {
        if h <= self.range {
            let r = h / self.range;
            return self.sill * (1.5 * r - 0.5 * r * r * r);
        }
        self.sill
    }
}
