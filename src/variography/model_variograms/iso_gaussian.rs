use super::IsoVariogramModel;

#[derive(Debug, Clone, Default, Copy, PartialEq)]
pub struct IsoGaussian {
    pub range: f64,
    pub sill: f64,
}

impl IsoGaussian {
    pub fn new(range: f64, sill: f64) -> Self {
        Self { range, sill }
    }
}

impl IsoVariogramModel for IsoGaussian {
    fn c_0(&self) -> f64 {
        self.sill
    }

    fn variogram(&self, h: f64) -> f64 {
        let r = h / self.range;
        self.sill * (1.0 - (-r * r).exp())
    }
}
