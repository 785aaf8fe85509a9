#![no_main]

use libfuzzer_sys::fuzz_target;
use lx_array::{NdArray, shift_source};
use lx_expr::{Context, ContextValue, source};
use lx_types::Scalar;

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let rows = usize::from(data[0] % 4) + 1;
    let amount = i64::from(data[1] as i8);
    let axis = usize::from(data[2] % 3);
    let fill = i64::from(data[3] as i8);
    let values: Vec<Scalar> = data[4..]
        .iter()
        .map(|byte| Scalar::Int64(i64::from(*byte as i8)))
        .collect();
    let cols = values.len() / rows;
    if cols == 0 {
        return;
    }
    let values = values[..rows * cols].to_vec();
    let Ok(array) = NdArray::from_shape_scalars(&[rows, cols], values.clone()) else {
        return;
    };

    let ctx = Context::single(ContextValue::array(array));
    let Ok(out) = source(0).shift_along(amount, fill, axis).eval(&ctx, None) else {
        assert!(axis >= 2, "only the out-of-range axis may fail");
        return;
    };
    let Some(out) = out.as_array() else {
        panic!("array input must stay an array");
    };
    assert_eq!(out.shape(), &[rows, cols]);

    let shifted = out.to_scalars();
    for row in 0..rows {
        for col in 0..cols {
            let from = if axis == 0 {
                shift_source(row, amount, rows).map(|r| r * cols + col)
            } else {
                shift_source(col, amount, cols).map(|c| row * cols + c)
            };
            let expected = from.map_or(Scalar::Int64(fill), |index| values[index].clone());
            assert_eq!(shifted[row * cols + col], expected);
        }
    }
});
