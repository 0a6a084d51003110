//! 物体検出の結果を表すモジュール

/// フレームのピクセル座標系での軸平行な矩形
///
/// 座標は負の値やフレーム外の値をとることがあります。クリッピングは描画側で行います。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BoundingBox {
    /// 左端のx
    pub left: i32,
    /// 上端のy
    pub top: i32,
    /// 右端のx
    pub right: i32,
    /// 下端のy
    pub bottom: i32,
}

impl BoundingBox {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    /// 面積。幅か高さが負の矩形は 0 とします。
    pub fn area(&self) -> i64 {
        i64::from(self.width().max(0)) * i64::from(self.height().max(0))
    }

    /// 2 つの矩形の共通部分。重ならない場合は `None` を返します。
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        if left >= right || top >= bottom {
            return None;
        }
        Some(Self::new(left, top, right, bottom))
    }
}

/// ネットワークが検出した物体
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    /// ラベルリストのインデックス
    pub class_id: usize,
    /// ラベル名
    pub class_name: String,
    /// バウンディングボックス
    pub bounding_box: BoundingBox,
    /// コンフィデンス
    pub confidence: f32,
}
