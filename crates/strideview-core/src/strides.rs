use crate::{RVec, Shape};

/// Per-axis element strides.
///
/// A stride of 0 replays the same element along the axis (broadcasting),
/// negative strides walk the axis backwards.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Strides(RVec<isize>);

impl Strides {
    pub fn to_vec(&self) -> Vec<isize> {
        self.0.to_vec()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &isize> {
        self.0.iter()
    }

    pub fn push(&mut self, stride: isize) {
        self.0.push(stride);
    }

    pub fn last(&self) -> Option<&isize> {
        self.0.last()
    }

    pub fn drop_dims(&self, drop: &[bool]) -> Self {
        Strides(
            self.0
                .iter()
                .zip(drop.iter())
                .filter_map(|(&s, &dropped)| (!dropped).then_some(s))
                .collect(),
        )
    }
}

impl std::fmt::Debug for Strides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(first) = self.0.first() else {
            return write!(f, "[]");
        };
        let mut shape = format!("[{}", first);
        for dim in self.0.iter().skip(1) {
            shape.push_str(&format!("x{}", dim));
        }
        write!(f, "{}]", shape)
    }
}

/// Dense strides with axis 0 varying fastest.
impl From<&Shape> for Strides {
    fn from(shape: &Shape) -> Self {
        let mut strides = RVec::with_capacity(shape.rank());
        let mut stride = 1;
        for size in shape.iter() {
            strides.push(stride);
            stride *= *size as isize;
        }
        Self(strides)
    }
}

impl From<Vec<isize>> for Strides {
    fn from(strides: Vec<isize>) -> Self {
        Self(strides.into())
    }
}

impl std::ops::Index<usize> for Strides {
    type Output = isize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for Strides {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use crate::shape;

    #[test]
    fn test_strides() {
        use super::*;
        let shape = shape![2, 3, 4];
        let strides = Strides::from(&shape);
        assert_eq!(strides.to_vec(), vec![1, 2, 6]);
    }

    #[test]
    fn test_drop_dims() {
        use super::*;
        let strides = Strides::from(vec![1, 0, 6]);
        assert_eq!(strides.drop_dims(&[false, true, false]).to_vec(), vec![1, 6]);
    }
}
