//! Insertion-sorted vector with a contextful comparator and position tracking
//!
//! The elements are kept in non-decreasing order. An element inserted next to
//! equal elements is placed after them, so elements with equal keys come out
//! in insertion order.
//!
//! Both operations are *O(n)*. This is meant for a small `n`, where the
//! simplicity of a fully-sorted array (the minimum is always at index `0`,
//! removal by position is a plain shift) outweighs the asymptotic advantage of
//! a binary heap.
mod veclike;
pub use self::veclike::*;

/// Context type for [`SortedVec`]'s operations.
pub trait SortedVecCtx<Element> {
    /// Return `true` iff `x < y`.
    fn lt(&mut self, x: &Element, y: &Element) -> bool;

    /// Called when the element `e` is moved to the new position `new_index`.
    fn on_move(&mut self, e: &mut Element, new_index: usize) {
        let _ = (e, new_index);
    }
}

impl<T: Ord> SortedVecCtx<T> for () {
    fn lt(&mut self, x: &T, y: &T) -> bool {
        *x < *y
    }
}

/// Sorted vector.
pub trait SortedVec: VecLike {
    /// Insert an item and return its position. Returns the item back if the
    /// container is full.
    ///
    /// [`SortedVecCtx::on_move`] is called for the inserted item and for every
    /// item shifted to make room for it.
    fn sorted_insert(
        &mut self,
        item: Self::Element,
        ctx: impl SortedVecCtx<Self::Element>,
    ) -> Result<usize, Self::Element>;

    /// Remove the item at the specified position and return it.
    ///
    /// [`SortedVecCtx::on_move`] is called for every item shifted to fill the
    /// gap. It's not called for the removed item.
    fn sorted_remove(
        &mut self,
        i: usize,
        ctx: impl SortedVecCtx<Self::Element>,
    ) -> Option<Self::Element>;

    /// Remove the least item and return it.
    fn sorted_pop_front(&mut self, ctx: impl SortedVecCtx<Self::Element>) -> Option<Self::Element> {
        self.sorted_remove(0, ctx)
    }
}

impl<T: VecLike> SortedVec for T {
    fn sorted_insert(
        &mut self,
        item: Self::Element,
        mut ctx: impl SortedVecCtx<Self::Element>,
    ) -> Result<usize, Self::Element> {
        if self.is_full() {
            return Err(item);
        }

        // Find the first element strictly greater than `item`. Stopping at
        // equal elements would break the FIFO order among ties.
        let i = self
            .iter()
            .position(|e| ctx.lt(&item, e))
            .unwrap_or(self.len());

        self.try_push(item)?;

        // Move the new item from the end to `i`, shifting the tail right
        let slice = &mut **self;
        slice[i..].rotate_right(1);

        for (pos, e) in slice.iter_mut().enumerate().skip(i) {
            ctx.on_move(e, pos);
        }

        Ok(i)
    }

    fn sorted_remove(
        &mut self,
        i: usize,
        mut ctx: impl SortedVecCtx<Self::Element>,
    ) -> Option<Self::Element> {
        if i >= self.len() {
            return None;
        }

        // Move the item at `i` to the end, shifting the tail left
        let slice = &mut **self;
        slice[i..].rotate_left(1);

        let item = self.pop();
        debug_assert!(item.is_some());

        for (pos, e) in self.iter_mut().enumerate().skip(i) {
            ctx.on_move(e, pos);
        }

        item
    }
}
