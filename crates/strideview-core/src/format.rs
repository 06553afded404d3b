use crate::{cpu::fetch, Shape, StorageError, Strides, TensorDType, TensorError, TensorView};

/// Controls [TensorView::as_string].
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_new::new)]
pub struct FormatOptions {
    /// Longer axes are elided in the middle.
    pub max_items: usize,
    /// Print the matrix level Matlab style, one row per line.
    pub column_major: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_items: 6,
            column_major: true,
        }
    }
}

struct Printer<'a, T> {
    data: &'a [T],
    dims: &'a Shape,
    strides: &'a Strides,
    opts: FormatOptions,
    out: String,
}

impl<T: TensorDType> Printer<'_, T> {
    fn push_n(&mut self, c: char, n: usize) {
        self.out.extend(std::iter::repeat(c).take(n));
    }

    /// Prints the sub-tensor of rank `sub_rank` starting at `pos`, which is item
    /// `index` along `axis` of its parent. Returns the next index to print.
    fn print(
        &mut self,
        pos: isize,
        sub_rank: usize,
        axis: usize,
        index: usize,
    ) -> Result<usize, StorageError> {
        let rank = self.dims.rank();
        let FormatOptions {
            max_items,
            column_major,
        } = self.opts;

        if index > 0 {
            let separator = if sub_rank == 1 && column_major { ';' } else { ',' };
            self.out.push(separator);
            self.push_n('\n', sub_rank);
            let indent = if sub_rank == 0 { 2 } else { rank - sub_rank };
            self.push_n(' ', indent);

            let len = self.dims[axis];
            if len > max_items && index == (max_items + 1) / 2 {
                if column_major && sub_rank == 1 {
                    self.out.push(' ');
                }
                self.out.push_str("...");
                return Ok(len - max_items / 2);
            }
        }

        if sub_rank == 0 {
            let value = fetch(self.data, pos)?;
            self.out.push_str(&value.to_string());
            return Ok(index + 1);
        }

        // the matrix level is transposed in column-major mode
        let axis1 = if rank >= 2 && sub_rank <= 2 && column_major {
            2 - sub_rank
        } else {
            sub_rank - 1
        };
        let bracketed = (!column_major || rank < 2 || sub_rank != 1) && rank > 0;
        if bracketed {
            self.out.push('[');
        }
        if sub_rank == 1 {
            self.out.push(' ');
        }
        let mut index1 = 0;
        while index1 < self.dims[axis1] {
            let at = pos + index1 as isize * self.strides[axis1];
            index1 = self.print(at, sub_rank - 1, axis1, index1)?;
        }
        if bracketed {
            if sub_rank == 1 || (column_major && sub_rank == 2) {
                self.out.push(' ');
            }
            self.out.push(']');
        }
        Ok(index + 1)
    }
}

impl<T: TensorDType> TensorView<T> {
    /// Renders the view's elements, eliding the middle of long axes.
    ///
    /// With `column_major`, a `[2 x 3]` matrix prints as `[ 1,  2,  3;\n  4,  5,  6 ]`.
    pub fn as_string(&self, opts: FormatOptions) -> Result<String, TensorError> {
        let data = self.sob().copy_to_vec();
        let mut printer = Printer {
            data: &data,
            dims: self.dims(),
            strides: self.shape().strides(),
            opts,
            out: String::with_capacity(self.shape().num_elements() * 5),
        };
        let rank = self.rank();
        printer.print(self.shape().offset() as isize, rank, rank, 0)?;
        Ok(printer.out)
    }
}

impl<T: TensorDType> std::fmt::Display for TensorView<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_string(FormatOptions::default()) {
            Ok(s) => write!(f, "{}", s),
            Err(e) => write!(f, "<{}>", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, Device, TensorShape};

    fn iota(dims: Shape) -> TensorView<f32> {
        let data = (0..dims.numel()).map(|v| v as f32).collect();
        TensorView::from_data(data, dims, Device::CPU).unwrap()
    }

    #[test]
    fn vector_with_ellipsis() {
        let v = iota(shape![10]);
        assert_eq!(v.to_string(), "[ 0,  1,  2,  ...,  7,  8,  9 ]");
        let short = iota(shape![3]);
        assert_eq!(short.to_string(), "[ 0,  1,  2 ]");
    }

    #[test]
    fn column_major_matrix() {
        let m = TensorView::from_data(vec![1f32, 4., 2., 5., 3., 6.], shape![2, 3], Device::CPU)
            .unwrap();
        assert_eq!(m.to_string(), "[ 1,  2,  3;\n  4,  5,  6 ]");
    }

    #[test]
    fn row_major_matrix() {
        let m = iota(shape![2, 2]);
        let s = m.as_string(FormatOptions::new(6, false)).unwrap();
        assert_eq!(s, "[[ 0,  1 ],\n [ 2,  3 ]]");
    }

    #[test]
    fn scalar_and_strided() {
        let s = TensorView::from_data(vec![7f32], shape![], Device::CPU).unwrap();
        assert_eq!(s.to_string(), "7");
        let m = iota(shape![2, 2]);
        let row = m
            .reviewed(TensorShape::new(shape![2], Strides::from(vec![2]), 1))
            .unwrap();
        assert_eq!(row.to_string(), "[ 1,  3 ]");
    }
}
